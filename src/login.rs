use crate::AuthorizationEndpoint;
use url::Url;

/// Everything that goes into an authorization request of the implicit flow.
#[derive(Debug, Clone)]
pub(crate) struct LoginUrlParams<'a> {
    pub response_type: &'a str,
    pub client_id: &'a str,
    pub state: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
    pub nonce: Option<&'a str>,
    pub login_hint: Option<&'a str>,
    pub prompt_none: bool,
    pub id_token_hint: Option<&'a str>,
    pub custom_query_params: &'a [(String, String)],
    pub params: &'a [(String, String)],
}

pub(crate) fn create_login_url(
    authorization_endpoint: AuthorizationEndpoint,
    params: &LoginUrlParams<'_>,
) -> Url {
    let mut login_url: Url = authorization_endpoint;
    {
        let mut query = login_url.query_pairs_mut();
        query
            .append_pair("response_type", params.response_type)
            .append_pair("client_id", params.client_id)
            .append_pair("state", params.state)
            .append_pair("redirect_uri", params.redirect_uri)
            .append_pair("scope", params.scope);
        if let Some(nonce) = params.nonce {
            query.append_pair("nonce", nonce);
        }
        if let Some(login_hint) = params.login_hint {
            query.append_pair("login_hint", login_hint);
        }
        if params.prompt_none {
            query.append_pair("prompt", "none");
        }
        if let Some(id_token_hint) = params.id_token_hint {
            query.append_pair("id_token_hint", id_token_hint);
        }
        for (key, value) in params.custom_query_params.iter().chain(params.params) {
            query.append_pair(key, value);
        }
    }
    login_url
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertr::prelude::*;

    #[test]
    fn login_url_contains_parameters_in_order() {
        let custom = vec![("kc_idp_hint".to_owned(), "github".to_owned())];
        let extra = vec![("ui_locales".to_owned(), "de".to_owned())];
        let url = create_login_url(
            Url::parse("https://idp.example/auth").unwrap(),
            &LoginUrlParams {
                response_type: "id_token token",
                client_id: "app",
                state: "S1;data",
                redirect_uri: "https://app.example/callback",
                scope: "openid profile",
                nonce: Some("N"),
                login_hint: Some("user@idp.example"),
                prompt_none: true,
                id_token_hint: None,
                custom_query_params: &custom,
                params: &extra,
            },
        );

        assert_that(url.as_str()).is_equal_to(
            "https://idp.example/auth?response_type=id_token+token&client_id=app&state=S1%3Bdata\
             &redirect_uri=https%3A%2F%2Fapp.example%2Fcallback&scope=openid+profile&nonce=N\
             &login_hint=user%40idp.example&prompt=none&kc_idp_hint=github&ui_locales=de",
        );
    }

    #[test]
    fn optional_parameters_are_omitted() {
        let url = create_login_url(
            Url::parse("https://idp.example/auth").unwrap(),
            &LoginUrlParams {
                response_type: "token",
                client_id: "app",
                state: "S1",
                redirect_uri: "https://app.example/",
                scope: "api",
                nonce: None,
                login_hint: None,
                prompt_none: false,
                id_token_hint: None,
                custom_query_params: &[],
                params: &[],
            },
        );
        let keys = url.query_pairs().map(|(key, _)| key.into_owned()).collect::<Vec<_>>();
        assert_that(keys).is_equal_to(vec![
            "response_type".to_owned(),
            "client_id".to_owned(),
            "state".to_owned(),
            "redirect_uri".to_owned(),
            "scope".to_owned(),
        ]);
    }
}
